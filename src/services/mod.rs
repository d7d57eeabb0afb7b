pub mod gpa;
pub mod reconciler;

pub use gpa::GpaSummary;
pub use reconciler::{
    Attachment, CourseView, LinkState, MirrorEvent, PendingWrite, Reconciler, SubscriptionHandle,
};
