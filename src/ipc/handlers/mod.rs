pub mod assignments;
pub mod backup;
pub mod core;
pub mod local_records;
pub mod master_data;
pub mod non_local_records;
pub mod review;
pub mod users;
