pub mod ensemble;
