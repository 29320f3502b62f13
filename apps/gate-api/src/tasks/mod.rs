pub mod revalidation;
pub mod scheduler;
