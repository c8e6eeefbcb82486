pub mod doctor;
pub mod generate;
pub mod init;
pub mod install;
pub mod logs;
pub mod restart;
pub mod start;
pub mod status;
pub mod stop;
pub mod validate;
