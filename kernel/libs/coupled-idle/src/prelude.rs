// SPDX-License-Identifier: MPL-2.0

//! The prelude.

pub(crate) use alloc::{sync::Arc, vec::Vec};

pub(crate) use crate::{
    cpu::{CpuId, CpuSet},
    error::{Error, Result},
};
