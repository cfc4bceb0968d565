pub(crate) mod parser;
pub(crate) mod token;
