mod formula;
pub use formula::*;

pub(crate) use formula::is_element_symbol;
