mod rate_limit;
pub use rate_limit::*;

mod locks;
pub use locks::*;

mod approval;
pub use approval::*;

mod invoker;
pub use invoker::*;

mod orchestrator;
pub use orchestrator::*;

mod error;
pub use error::*;
