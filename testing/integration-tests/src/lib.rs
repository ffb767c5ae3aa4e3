// Copyright 2025 Farcall contributors.
// This file is dual-licensed as Apache-2.0 or GPL-3.0.
// see LICENSE for license details.

//! End-to-end tests for the farcall fabric: a real client and a real
//! server service, joined by an in-process loopback transport.

#[cfg(test)]
mod utils;

#[cfg(test)]
mod scenarios;

#[cfg(test)]
mod values;

#[cfg(test)]
mod downstream;
