//! Row decoding: column lookup (named, falling back to positional),
//! scalar/array/JSON text-format decoding, and compile-time enum mapping.

use std::sync::Arc;

use bytes::Bytes;

use crate::message::{DataRow, FieldDescription};

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub name: String,
    pub normalized_name: String,
    pub type_oid: u32,
}

/// Lowercase, map every non `[a-z0-9]` byte to `_`, and collapse runs of
/// `_` into one. Used so `"User Id"`, `"user_id"`, and `"USER-ID"` all key
/// the same column.
pub fn normalize_ident(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for c in name.chars() {
        let lc = c.to_ascii_lowercase();
        if lc.is_ascii_alphanumeric() {
            out.push(lc);
            prev_underscore = false;
        } else if !prev_underscore {
            out.push('_');
            prev_underscore = true;
        }
    }
    out
}

pub fn columns_from_fields(fields: &[FieldDescription]) -> Arc<[ColumnInfo]> {
    fields
        .iter()
        .map(|f| ColumnInfo {
            name: f.name.clone(),
            normalized_name: normalize_ident(&f.name),
            type_oid: f.type_oid,
        })
        .collect()
}

#[derive(Clone)]
pub struct PgRow {
    columns: Arc<[ColumnInfo]>,
    values: Vec<Option<Bytes>>,
}

impl PgRow {
    pub fn from_data_row(columns: Arc<[ColumnInfo]>, data: DataRow) -> Self {
        PgRow {
            columns,
            values: data.values,
        }
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The raw text-format bytes for a column, or `None` if the value was SQL
    /// `NULL`. Looking a name up that matches no column (by normalized name)
    /// then fails to parse as a positional index is the one case this
    /// returns an error rather than `None`/`Some`.
    pub fn try_get_raw(&self, index: impl ColumnIndex) -> crate::Result<Option<&[u8]>> {
        let i = index.resolve(&self.columns)?;
        Ok(self.values[i].as_deref())
    }

    pub fn try_get<T: Decode>(&self, index: impl ColumnIndex) -> crate::Result<T> {
        T::decode(self.try_get_raw(index)?)
    }

    pub fn get<T: Decode>(&self, index: impl ColumnIndex) -> T {
        self.try_get(index).expect("column index/decode failed")
    }
}

impl std::fmt::Debug for PgRow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgRow")
            .field("columns", &self.columns.len())
            .finish()
    }
}

/// Resolves a column reference against a row's column list. Implemented for
/// `usize` (direct positional access) and `&str` (normalized-name lookup,
/// falling back to parsing the string itself as a positional index).
pub trait ColumnIndex {
    fn resolve(&self, columns: &[ColumnInfo]) -> crate::Result<usize>;
}

impl ColumnIndex for usize {
    fn resolve(&self, columns: &[ColumnInfo]) -> crate::Result<usize> {
        if *self >= columns.len() {
            return Err(crate::err_protocol!(
                "column index {self} out of range (row has {} columns)",
                columns.len()
            ));
        }
        Ok(*self)
    }
}

impl ColumnIndex for &str {
    fn resolve(&self, columns: &[ColumnInfo]) -> crate::Result<usize> {
        let wanted = normalize_ident(self);
        if let Some(pos) = columns.iter().position(|c| c.normalized_name == wanted) {
            return Ok(pos);
        }
        if let Ok(i) = self.parse::<usize>() {
            return i.resolve(columns);
        }
        Err(crate::err_protocol!("no column named {self:?}"))
    }
}

/// Decode a column's text-format wire value. `raw` is `None` for SQL `NULL`.
pub trait Decode: Sized {
    fn decode(raw: Option<&[u8]>) -> crate::Result<Self>;
}

macro_rules! impl_decode_via_from_str {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl Decode for $ty {
                fn decode(raw: Option<&[u8]>) -> crate::Result<Self> {
                    let raw = raw.ok_or_else(|| crate::err_protocol!(
                        concat!("unexpected NULL for ", stringify!($ty), " column")
                    ))?;
                    let s = std::str::from_utf8(raw)
                        .map_err(|e| crate::err_protocol!("invalid UTF-8 in column value: {e}"))?;
                    s.parse::<$ty>()
                        .map_err(|e| crate::err_protocol!("failed to parse {s:?} as {}: {e}", stringify!($ty)))
                }
            }
        )+
    };
}

impl_decode_via_from_str!(i16, i32, i64, f32, f64);

impl Decode for bool {
    fn decode(raw: Option<&[u8]>) -> crate::Result<Self> {
        let raw = raw.ok_or_else(|| crate::err_protocol!("unexpected NULL for bool column"))?;
        match raw {
            b"t" => Ok(true),
            b"f" => Ok(false),
            other => Err(crate::err_protocol!(
                "invalid bool text representation: {:?}",
                String::from_utf8_lossy(other)
            )),
        }
    }
}

impl Decode for String {
    fn decode(raw: Option<&[u8]>) -> crate::Result<Self> {
        let raw = raw.ok_or_else(|| crate::err_protocol!("unexpected NULL for text column"))?;
        Ok(String::from_utf8_lossy(raw).into_owned())
    }
}

impl Decode for Vec<u8> {
    fn decode(raw: Option<&[u8]>) -> crate::Result<Self> {
        let raw = raw.ok_or_else(|| crate::err_protocol!("unexpected NULL for bytea column"))?;
        let hex = std::str::from_utf8(raw)
            .ok()
            .and_then(|s| s.strip_prefix("\\x"))
            .ok_or_else(|| crate::err_protocol!("expected \\x-prefixed bytea text encoding"))?;
        decode_hex(hex)
    }
}

fn decode_hex(hex: &str) -> crate::Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(crate::err_protocol!("odd-length bytea hex payload"));
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&hex[i..i + 2], 16)
                .map_err(|e| crate::err_protocol!("invalid bytea hex digit: {e}"))
        })
        .collect()
}

impl<T: Decode> Decode for Option<T> {
    fn decode(raw: Option<&[u8]>) -> crate::Result<Self> {
        match raw {
            None => Ok(None),
            Some(_) => T::decode(raw).map(Some),
        }
    }
}

impl<T> Decode for Vec<T>
where
    T: Decode,
{
    fn decode(raw: Option<&[u8]>) -> crate::Result<Self> {
        let raw = raw.ok_or_else(|| crate::err_protocol!("unexpected NULL for array column"))?;
        let literal = std::str::from_utf8(raw)
            .map_err(|e| crate::err_protocol!("invalid UTF-8 in array literal: {e}"))?;
        let elements = parse_pg_array(literal)?;
        elements
            .into_iter()
            .map(|el| T::decode(el.as_deref().map(str::as_bytes)))
            .collect()
    }
}

/// Parse a one-dimensional PostgreSQL array literal (`{1,2,NULL,"a,b"}`)
/// into its elements, unescaping quoted values and mapping bare `NULL`
/// tokens to `None`.
pub fn parse_pg_array(literal: &str) -> crate::Result<Vec<Option<String>>> {
    let s = literal.trim();
    let inner = s
        .strip_prefix('{')
        .and_then(|s| s.strip_suffix('}'))
        .ok_or_else(|| crate::err_protocol!("invalid array literal: {literal}"))?;

    if inner.is_empty() {
        return Ok(Vec::new());
    }

    let mut elements = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    let mut was_quoted = false;
    let mut chars = inner.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                quoted = !quoted;
                was_quoted = true;
            }
            '\\' if quoted => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            ',' if !quoted => {
                elements.push(take_array_element(&mut current, &mut was_quoted));
            }
            other => current.push(other),
        }
    }
    elements.push(take_array_element(&mut current, &mut was_quoted));

    Ok(elements)
}

fn take_array_element(current: &mut String, was_quoted: &mut bool) -> Option<String> {
    let value = std::mem::take(current);
    let quoted = std::mem::replace(was_quoted, false);
    if !quoted && value.eq_ignore_ascii_case("null") {
        None
    } else {
        Some(value)
    }
}

/// Render elements back into PostgreSQL array literal syntax, for use as a
/// text-format `Bind` parameter. An element is double-quoted only when it
/// needs to be: when it contains a delimiter/quote/backslash or whitespace,
/// is empty, or would otherwise read back as the bare `NULL` marker.
pub fn encode_pg_array<'a>(elements: impl IntoIterator<Item = Option<&'a str>>) -> String {
    let mut out = String::from("{");
    let mut first = true;
    for el in elements {
        if !first {
            out.push(',');
        }
        first = false;
        match el {
            None => out.push_str("NULL"),
            Some(value) => {
                if needs_array_quoting(value) {
                    out.push('"');
                    for c in value.chars() {
                        if c == '"' || c == '\\' {
                            out.push('\\');
                        }
                        out.push(c);
                    }
                    out.push('"');
                } else {
                    out.push_str(value);
                }
            }
        }
    }
    out.push('}');
    out
}

fn needs_array_quoting(value: &str) -> bool {
    value.is_empty()
        || value.eq_ignore_ascii_case("null")
        || value
            .chars()
            .any(|c| matches!(c, ',' | '{' | '}' | '"' | '\\') || c.is_whitespace())
}

#[cfg(feature = "json")]
impl Decode for serde_json::Value {
    fn decode(raw: Option<&[u8]>) -> crate::Result<Self> {
        let raw = raw.ok_or_else(|| crate::err_protocol!("unexpected NULL for JSON column"))?;
        serde_json::from_slice(raw).map_err(|e| crate::err_protocol!("invalid JSON: {e}"))
    }
}

/// A JSON column decoded leniently: a malformed payload yields `None`
/// instead of failing the whole row.
#[cfg(feature = "json")]
pub struct LenientJson(pub Option<serde_json::Value>);

#[cfg(feature = "json")]
impl Decode for LenientJson {
    fn decode(raw: Option<&[u8]>) -> crate::Result<Self> {
        Ok(LenientJson(match raw {
            None => None,
            Some(bytes) => serde_json::from_slice(bytes).ok(),
        }))
    }
}

/// Decodes a whole row into an aggregate type, trying column-name matching
/// first and falling back to positional (column 0 → field 0, ...) only when
/// not every field has a matching column. Implement via [`pg_from_row!`]
/// rather than by hand.
///
/// This is the whole-row analogue of [`ColumnIndex`]: `ColumnIndex` resolves
/// one field at a time and always accepts a name-or-position argument from
/// the caller, whereas `FromRow` decides, once per row, whether the *entire*
/// struct can be matched by name before falling back, so a client stays
/// correct whether the query was `SELECT *` (stable names, maybe reordered)
/// or `SELECT a, b, c` (stable order, names that may not be present at all,
/// e.g. an expression column).
pub trait FromRow: Sized {
    fn from_row(row: &PgRow) -> crate::Result<Self>;
}

/// Resolve every name in `names` against `row`'s columns by normalized name,
/// returning `None` (rather than a partial result) the moment one fails to
/// match, since a partial name match isn't a usable mode — the caller should
/// fall back to positional decoding entirely in that case.
pub fn resolve_named(row: &PgRow, names: &[&str]) -> Option<Vec<usize>> {
    let mut indices = Vec::with_capacity(names.len());
    for name in names {
        let wanted = normalize_ident(name);
        let pos = row.columns().iter().position(|c| c.normalized_name == wanted)?;
        indices.push(pos);
    }
    Some(indices)
}

/// Decode every row in `rows` via [`FromRow`], stopping at the first error.
pub fn decode_rows<T: FromRow>(rows: &[PgRow]) -> crate::Result<Vec<T>> {
    rows.iter().map(T::from_row).collect()
}

/// Declares a [`FromRow`] impl for a plain struct: tries to resolve every
/// named field against the row's columns first (the `SELECT *`-friendly
/// path); if any field name has no matching column, re-decodes every field
/// positionally by declaration order instead (the `SELECT a, b, c` path).
///
/// ```ignore
/// struct User { id: i64, name: String }
/// pg_from_row!(User { id: i64, name: String });
/// ```
#[macro_export]
macro_rules! pg_from_row {
    ($ty:ty { $($field:ident: $fty:ty),+ $(,)? }) => {
        impl $crate::row::FromRow for $ty {
            fn from_row(row: &$crate::row::PgRow) -> $crate::Result<Self> {
                const FIELD_NAMES: &[&str] = &[$(stringify!($field)),+];

                if let Some(indices) = $crate::row::resolve_named(row, FIELD_NAMES) {
                    let mut positions = indices.into_iter();
                    return Ok(Self {
                        $($field: row.try_get::<$fty>(positions.next().expect("one index per field"))?,)+
                    });
                }

                let mut __pg_pos = 0usize;
                $(
                    let $field: $fty = row.try_get(__pg_pos)?;
                    #[allow(unused_assignments)]
                    { __pg_pos += 1; }
                )+
                Ok(Self { $($field),+ })
            }
        }
    };
}

/// Maps a Rust enum to/from its PostgreSQL text representation through a
/// compile-time `{value -> string}` table. Implement via [`pg_enum!`].
pub trait PgEnum: Sized + Copy {
    const VARIANTS: &'static [(&'static str, Self)];

    fn from_wire(value: &str) -> crate::Result<Self> {
        if let Some((_, variant)) = Self::VARIANTS.iter().find(|(text, _)| *text == value) {
            return Ok(*variant);
        }
        // Fall back to treating the text as the variant's ordinal index,
        // for enums whose server-side representation is integer-backed.
        if let Ok(ordinal) = value.parse::<usize>() {
            if let Some((_, variant)) = Self::VARIANTS.get(ordinal) {
                return Ok(*variant);
            }
        }
        Err(crate::err_protocol!("unknown enum value: {value:?}"))
    }

    fn to_wire(&self) -> &'static str {
        Self::VARIANTS
            .iter()
            .find(|(_, v)| std::mem::discriminant(v) == std::mem::discriminant(self))
            .map(|(text, _)| *text)
            .unwrap_or("")
    }
}

/// Declares a [`PgEnum`] impl for a plain enum with a `{variant => "text"}`
/// table (plus the integer-ordinal fallback for decoding), and wires it up
/// to [`Decode`] and [`crate::encode::Encode`] directly.
///
/// `Decode`/`Encode` are implemented per concrete enum type here rather than
/// via a blanket `impl<T: PgEnum> Decode for T`: a blanket impl over an
/// unconstrained `T` would conflict with the `Vec<T>`/`Option<T>` blanket
/// impls of the same traits, since the compiler can't rule out some future
/// `PgEnum` impl for `Vec<_>`/`Option<_>` overlapping with them.
#[macro_export]
macro_rules! pg_enum {
    ($ty:ty { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $crate::row::PgEnum for $ty {
            const VARIANTS: &'static [(&'static str, Self)] = &[
                $(($text, <$ty>::$variant)),+
            ];
        }

        impl $crate::row::Decode for $ty {
            fn decode(raw: Option<&[u8]>) -> $crate::Result<Self> {
                let raw = raw.ok_or_else(|| {
                    $crate::err_protocol!("unexpected NULL for enum column")
                })?;
                let s = std::str::from_utf8(raw).map_err(|e| {
                    $crate::err_protocol!("invalid UTF-8 in enum value: {e}")
                })?;
                <$ty as $crate::row::PgEnum>::from_wire(s)
            }
        }

        impl $crate::encode::Encode for $ty {
            const OID: u32 = 25;

            fn encode_text(&self) -> Option<String> {
                Some(<$ty as $crate::row::PgEnum>::to_wire(self).to_string())
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_mixed_case_and_punctuation() {
        assert_eq!(normalize_ident("User Id"), "user_id");
        assert_eq!(normalize_ident("USER--ID"), "user_id");
        assert_eq!(normalize_ident("already_snake"), "already_snake");
    }

    #[test]
    fn parses_simple_int_array() {
        let elements = parse_pg_array("{1,2,3}").unwrap();
        assert_eq!(
            elements,
            vec![Some("1".into()), Some("2".into()), Some("3".into())]
        );
    }

    #[test]
    fn parses_array_with_null_and_quoted_comma() {
        let elements = parse_pg_array(r#"{NULL,"a,b","with \"quote\""}"#).unwrap();
        assert_eq!(
            elements,
            vec![None, Some("a,b".into()), Some("with \"quote\"".into())]
        );
    }

    #[test]
    fn empty_array_literal_has_no_elements() {
        assert_eq!(parse_pg_array("{}").unwrap(), Vec::<Option<String>>::new());
    }

    #[test]
    fn round_trips_through_encode_and_parse() {
        let encoded = encode_pg_array(vec![Some("a"), None, Some("b,c")]);
        let decoded = parse_pg_array(&encoded).unwrap();
        assert_eq!(decoded, vec![Some("a".into()), None, Some("b,c".into())]);
    }

    #[test]
    fn decodes_bytea_hex_encoding() {
        let bytes: Vec<u8> = Decode::decode(Some(b"\\xdeadbeef")).unwrap();
        assert_eq!(bytes, vec![0xde, 0xad, 0xbe, 0xef]);
    }

    #[derive(Debug, PartialEq)]
    struct Account {
        id: i64,
        name: String,
    }

    crate::pg_from_row!(Account { id: i64, name: String });

    fn row_with(columns: &[&str], values: &[Option<&str>]) -> PgRow {
        let columns: Arc<[ColumnInfo]> = columns
            .iter()
            .map(|name| ColumnInfo {
                name: (*name).to_string(),
                normalized_name: normalize_ident(name),
                type_oid: 0,
            })
            .collect();
        let values = values
            .iter()
            .map(|v| v.map(|s| Bytes::copy_from_slice(s.as_bytes())))
            .collect();
        PgRow { columns, values }
    }

    #[test]
    fn from_row_matches_by_name_regardless_of_column_order() {
        let row = row_with(&["name", "id"], &[Some("bob"), Some("7")]);
        let account = Account::from_row(&row).unwrap();
        assert_eq!(
            account,
            Account {
                id: 7,
                name: "bob".into()
            }
        );
    }

    #[test]
    fn from_row_falls_back_to_positional_when_a_name_is_missing() {
        // e.g. `SELECT id, name_of_account` — no column named "name" exists,
        // so the whole row decodes positionally instead of per-field.
        let row = row_with(&["id", "name_of_account"], &[Some("9"), Some("carol")]);
        let account = Account::from_row(&row).unwrap();
        assert_eq!(
            account,
            Account {
                id: 9,
                name: "carol".into()
            }
        );
    }

    #[test]
    fn normalize_ident_is_idempotent() {
        for input in ["User Id", "already_snake", "A--B__C", ""] {
            let once = normalize_ident(input);
            let twice = normalize_ident(&once);
            assert_eq!(once, twice);
        }
    }
}
