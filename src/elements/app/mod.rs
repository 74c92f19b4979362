//! Elements connecting a pipeline to application code.

mod appsink;

pub use appsink::AppSink;
