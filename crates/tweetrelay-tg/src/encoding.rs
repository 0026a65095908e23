use crate::util::prelude::*;
use serde::Serialize;
use std::any::type_name;

pub(crate) fn to_json_string_pretty<T: Serialize + ?Sized>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|err| {
        panic!(
            "Can't serialize data of type {}: {}",
            type_name::<T>(),
            err.display_chain()
        )
    })
}
