pub mod decay;
pub mod model;
pub mod ou_process;
pub mod reaction_network;
