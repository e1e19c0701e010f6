pub mod assignment;
pub mod class_group;
pub mod course;

pub use assignment::{AssignmentRequest, CourseAssignment, MergeOp, SyncRecord};
pub use class_group::{AddStudentRequest, ClassGroup, ClassView, FanoutResult, NewClassRequest};
pub use course::{Course, CourseUpsert, CourseView, NewCourseRequest, UpdateCourseRequest, union_ordered};
