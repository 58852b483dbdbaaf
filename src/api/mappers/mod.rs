// Protocol mappers: public request/response shapes <-> upstream

pub mod claude;
pub mod common_utils;
pub mod gemini;
pub mod openai;
pub mod upstream;
