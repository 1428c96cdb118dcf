pub mod attempt_dto;
pub mod exam_dto;
pub mod public_dto;
pub mod student_dto;
