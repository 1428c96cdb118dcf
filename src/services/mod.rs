pub mod ai_service;
pub mod analysis_service;
pub mod artifact_service;
pub mod attempt_service;
pub mod exam_service;
pub mod grading_service;
pub mod report_service;
pub mod student_service;
