pub mod attempt;
pub mod exam;
pub mod question;
pub mod report;
pub mod student;
