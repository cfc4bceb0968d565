pub(crate) mod board;
pub(crate) mod direction;
pub(crate) mod game;
pub(crate) mod legal;
