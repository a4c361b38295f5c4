pub mod assignment;
pub mod conf_space;
pub mod ids;
