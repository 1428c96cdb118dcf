pub mod attempts;
pub mod exams;
pub mod health;
pub mod public;
pub mod reports;
pub mod students;
