mod category;
mod job;
mod result;

pub use category::ResultCategory;
pub use job::{DecodeError, JobMessage, JobType};
pub use result::{ResultMessage, ResultStatus};
