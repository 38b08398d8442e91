// Organising pipeline: hash, date, dedup, place.

pub mod date;
pub mod dedup;
pub mod exif;
pub mod fingerprint;
pub mod keywords;
pub mod organizer;
pub mod scanner;
