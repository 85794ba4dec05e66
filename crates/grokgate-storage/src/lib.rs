pub mod db;
pub mod entities;
mod seaorm;

pub use db::connect_shared;
pub use seaorm::SeaOrmCredentialStore;
