pub mod table;

pub use table::{RouteMatch, RouteTable};
