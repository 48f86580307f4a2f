pub mod ri5;
pub mod root_finder;
pub mod stages;
pub mod tableau;
pub mod validity;
