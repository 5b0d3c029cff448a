pub mod lru_cascade;
