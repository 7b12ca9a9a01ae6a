mod common;
mod upgrades;
