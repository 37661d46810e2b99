pub mod measurements;
pub mod players;
pub mod sensor_data;
