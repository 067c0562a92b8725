macro_rules! dyn_map_fun {
    ($value:expr, $enum:ident, $fun:ident $(, $arg:expr)*) => {
        match $value {
            $enum::I8(_val) => _val.$fun($($arg),*),
            $enum::I16(_val) => _val.$fun($($arg),*),
            $enum::I32(_val) => _val.$fun($($arg),*),
            $enum::I64(_val) => _val.$fun($($arg),*),
            $enum::U8(_val) => _val.$fun($($arg),*),
            $enum::U16(_val) => _val.$fun($($arg),*),
            $enum::U32(_val) => _val.$fun($($arg),*),
            $enum::U64(_val) => _val.$fun($($arg),*),
            $enum::F32(_val) => _val.$fun($($arg),*),
            $enum::F64(_val) => _val.$fun($($arg),*),
            $enum::Bool(_val) => _val.$fun($($arg),*),
            $enum::String(_val) => _val.$fun($($arg),*),
        }
    };
}

/// Evaluate `$body` with `$x` bound to the inner array of any numeric variant. `$other` is
/// evaluated for the remaining variants. Both branches must have the same type.
macro_rules! dyn_map_numeric {
    ($value:expr, $enum:ident, |$x:ident| $body:expr, $other:expr) => {
        match $value {
            $enum::I8($x) => $body,
            $enum::I16($x) => $body,
            $enum::I32($x) => $body,
            $enum::I64($x) => $body,
            $enum::U8($x) => $body,
            $enum::U16($x) => $body,
            $enum::U32($x) => $body,
            $enum::U64($x) => $body,
            $enum::F32($x) => $body,
            $enum::F64($x) => $body,
            _ => $other,
        }
    };
}

pub(crate) use {dyn_map_fun, dyn_map_numeric};
