//! Text-format parameter encoding for `Bind`, with OID inference so callers
//! never have to spell out a type OID by hand.

/// A value that can be sent as a `Bind` parameter. `OID` tells the server
/// how to interpret the text payload; `ARRAY_OID` is the OID of this type's
/// one-dimensional array, used when encoding a `Vec<Self>`.
pub trait Encode {
    const OID: u32;
    const ARRAY_OID: u32 = 0;

    /// `None` encodes as SQL `NULL`.
    fn encode_text(&self) -> Option<String>;
}

macro_rules! impl_encode_via_display {
    ($($ty:ty => ($oid:expr, $array_oid:expr)),+ $(,)?) => {
        $(
            impl Encode for $ty {
                const OID: u32 = $oid;
                const ARRAY_OID: u32 = $array_oid;

                fn encode_text(&self) -> Option<String> {
                    Some(self.to_string())
                }
            }
        )+
    };
}

impl_encode_via_display!(
    i16 => (21, 1005),
    i32 => (23, 1007),
    i64 => (20, 1016),
    f32 => (700, 1021),
    f64 => (701, 1022),
);

impl Encode for bool {
    const OID: u32 = 16;
    const ARRAY_OID: u32 = 1000;

    fn encode_text(&self) -> Option<String> {
        Some(if *self { "t".to_string() } else { "f".to_string() })
    }
}

impl Encode for str {
    const OID: u32 = 25;
    const ARRAY_OID: u32 = 1009;

    fn encode_text(&self) -> Option<String> {
        Some(self.to_string())
    }
}

impl Encode for String {
    const OID: u32 = 25;
    const ARRAY_OID: u32 = 1009;

    fn encode_text(&self) -> Option<String> {
        Some(self.clone())
    }
}

impl Encode for &str {
    const OID: u32 = 25;
    const ARRAY_OID: u32 = 1009;

    fn encode_text(&self) -> Option<String> {
        Some((*self).to_string())
    }
}

impl Encode for Vec<u8> {
    const OID: u32 = 17;
    const ARRAY_OID: u32 = 1001;

    fn encode_text(&self) -> Option<String> {
        let mut out = String::with_capacity(2 + self.len() * 2);
        out.push_str("\\x");
        for b in self {
            out.push_str(&format!("{b:02x}"));
        }
        Some(out)
    }
}

impl<T: Encode> Encode for Option<T> {
    const OID: u32 = T::OID;
    const ARRAY_OID: u32 = T::ARRAY_OID;

    fn encode_text(&self) -> Option<String> {
        self.as_ref().and_then(Encode::encode_text)
    }
}

impl<T: Encode> Encode for Vec<T> {
    const OID: u32 = T::ARRAY_OID;

    fn encode_text(&self) -> Option<String> {
        let elements: Vec<Option<String>> = self.iter().map(Encode::encode_text).collect();
        Some(crate::row::encode_pg_array(
            elements.iter().map(|o| o.as_deref()),
        ))
    }
}

#[cfg(feature = "json")]
#[derive(Debug, Clone)]
pub struct Json(pub serde_json::Value);

#[cfg(feature = "json")]
impl Encode for Json {
    const OID: u32 = 114;

    fn encode_text(&self) -> Option<String> {
        Some(self.0.to_string())
    }
}

#[cfg(feature = "json")]
#[derive(Debug, Clone)]
pub struct Jsonb(pub serde_json::Value);

#[cfg(feature = "json")]
impl Encode for Jsonb {
    const OID: u32 = 3802;

    fn encode_text(&self) -> Option<String> {
        Some(self.0.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infers_scalar_oids() {
        assert_eq!(<i32 as Encode>::OID, 23);
        assert_eq!(<bool as Encode>::OID, 16);
        assert_eq!(<String as Encode>::OID, 25);
    }

    #[test]
    fn array_oid_comes_from_element_type() {
        assert_eq!(<Vec<i32> as Encode>::OID, 1007);
    }

    #[test]
    fn none_encodes_as_null() {
        let value: Option<i32> = None;
        assert_eq!(value.encode_text(), None);
    }

    #[test]
    fn array_round_trips_through_pg_array_syntax() {
        let values: Vec<i32> = vec![1, 2, 3];
        let encoded = values.encode_text().unwrap();
        assert_eq!(encoded, "{1,2,3}");
    }

    #[test]
    fn array_quotes_only_elements_that_need_it() {
        let values: Vec<String> = vec!["plain".into(), "needs,quoting".into()];
        let encoded = values.encode_text().unwrap();
        assert_eq!(encoded, r#"{plain,"needs,quoting"}"#);
    }
}
