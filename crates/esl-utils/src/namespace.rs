/// Stable diagnostic label for a registered event handler.
///
/// Dispatch failures are logged with this name rather than the raw address of
/// the handler, per the rule that handlers must expose a stable name instead
/// of relying on introspection tricks.
pub type HandlerName = String;

/// Return the short, unqualified name of type `T`, removing all module paths.
///
/// Example: `my_crate::handlers::SofiaPreRegister` -> `"SofiaPreRegister"`.
/// Used as the default label for handlers registered without an explicit
/// name.
#[inline]
pub fn short_typename<T>() -> HandlerName {
    let s = std::any::type_name::<T>();
    let mut out = String::with_capacity(32);
    let bytes = s.as_bytes();
    let mut seg_start = 0usize;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b'<' | b',' | b'>' => {
                if seg_start < i {
                    let seg = s[seg_start..i].trim();
                    if !seg.is_empty() {
                        out.push_str(seg.rsplit("::").next().unwrap_or(seg));
                    }
                }
                out.push(b as char);
                if b == b',' {
                    out.push(' ');
                }
                seg_start = i + 1;
            }
            _ => {}
        }
    }

    if seg_start < s.len() {
        let seg = s[seg_start..].trim();
        if !seg.is_empty() {
            out.push_str(seg.rsplit("::").next().unwrap_or(seg));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::short_typename;

    struct SofiaPreRegister;

    #[test]
    fn strips_module_path() {
        assert_eq!(short_typename::<SofiaPreRegister>(), "SofiaPreRegister");
    }

    #[test]
    fn strips_generic_args() {
        assert_eq!(short_typename::<Option<SofiaPreRegister>>(), "Option<SofiaPreRegister>");
    }
}
