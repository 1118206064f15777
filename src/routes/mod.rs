pub mod customers;
pub mod orders;
pub mod vendors;
