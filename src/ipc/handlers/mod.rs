pub mod assignments;
pub mod classes;
pub mod core;
pub mod exams;
pub mod grades;
pub mod lessons;
pub mod students;
pub mod subjects;
pub mod teachers;
