mod helpers;

mod cache;
mod composite;
mod quota;
mod refresh;
