//! wasm-bindgen surface for browser hosts: a stateless engine call per
//! request, the page owns the game state.

use wasm_bindgen::prelude::*;

use crate::engines::{ChessEngine, MinMaxEngine};

#[wasm_bindgen]
pub fn get_move(fen: String) -> Result<String, JsError> {
    MinMaxEngine::default()
        .compute_move(&fen)
        .map_err(|e| JsError::new(&e.to_string()))
}

#[wasm_bindgen]
pub fn get_eval(fen: String) -> Result<i32, JsError> {
    MinMaxEngine::default()
        .evaluate(&fen)
        .map_err(|e| JsError::new(&e.to_string()))
}
