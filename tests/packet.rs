//
// Copyright (c) The BFD Engine Contributors
//
// SPDX-License-Identifier: MIT
//

#[path = "packet/mod.rs"]
mod packet;
