pub mod feedback;
pub mod registration;
pub mod scan;
pub mod worker;
