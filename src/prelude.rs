pub(crate) use crate::{
    error::{Errno::*, Error},
    return_errno_with_msg,
};

pub(crate) type Result<T> = core::result::Result<T, Error>;

pub(crate) use core::fmt::{self, Debug};

#[allow(unused_imports)]
pub(crate) use log::{debug, info, warn};
