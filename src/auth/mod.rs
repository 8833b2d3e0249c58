// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Credential extraction.
//!
//! There is no password or token-introspection step here: the bearer
//! credential *is* the identity, and turning it into a user is the session
//! resolver's job. This module only pulls the raw credential out of the
//! request.

pub mod extractor;

pub use extractor::Credential;
