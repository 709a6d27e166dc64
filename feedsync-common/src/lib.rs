pub mod identity;
pub mod model;
pub mod util;
