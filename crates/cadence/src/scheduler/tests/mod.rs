pub(crate) mod common;

mod dispatch;
mod due;
mod eligibility;
mod template;
