pub mod backup;
pub mod classes;
pub mod core;
pub mod exchange;
pub mod rooms;
pub mod seating;
pub mod students;
