pub mod driver;
pub mod mock_data_generator;

pub use driver::MockDriver;
pub use mock_data_generator::EegGenerator;
