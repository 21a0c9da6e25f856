//! Change transaction dispatch: classifying transactions into actions and turning actions into
//! ordered row operations.

mod action;
mod data;
mod dispatcher;
mod rows;

pub use action::{ActionContext, LoadAction, PkGenerator, PkRule, TransformAction, prepare};
pub use data::LoadData;
pub use dispatcher::{TxActions, TxTransform};
pub use rows::TxRowGenerator;
