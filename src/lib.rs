pub mod models {
    pub mod occupancy;
    pub mod occupeye;
}

pub mod auth;
pub mod client;
pub mod codec;
pub mod config;
pub mod keys;
pub mod store;
pub mod utils;
pub mod services {
    pub mod history;
    pub mod query;
    pub mod refresh;
}

#[cfg(test)]
mod test_support;
