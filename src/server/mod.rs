mod http;

pub use http::{Server, build_router};
