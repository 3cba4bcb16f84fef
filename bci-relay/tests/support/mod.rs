mod fake_board;

pub use fake_board::{ Call, FakeBoard };
