//! Outer adapters: how catalogs and command sessions come in and how machine
//! status goes out.

pub mod csv;
