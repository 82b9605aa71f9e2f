//! SQL helpers shared by the relational adapters.

pub mod booleans;
pub mod quote;
pub mod result;

pub use booleans::BooleanConvention;
pub use quote::{
    quote_ident, quote_ident_always, quote_literal, quote_literal_list, quote_qualified,
};
pub use result::{get_single_int, get_single_time, parse_single_value, ResultSet, Value};
