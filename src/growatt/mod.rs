pub mod frame;
pub mod packet;
