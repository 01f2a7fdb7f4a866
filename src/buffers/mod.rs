pub mod buffer_pool;
pub mod fixed_buffer;
pub mod packet_buf;
