pub mod invoker;

pub use invoker::TransformInvoker;
