pub mod capabilities;
pub mod chat;
pub mod init;
pub mod serve;
