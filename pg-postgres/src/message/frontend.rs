use super::codec::{write_framed, write_framed_untyped};

pub trait FrontendMessage {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()>;
}

fn put_cstr(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

pub struct Startup<'a> {
    pub username: Option<&'a str>,
    pub database: Option<&'a str>,
    pub params: &'a [(&'a str, &'a str)],
}

impl FrontendMessage for Startup<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        write_framed_untyped(buf, |buf| {
            buf.extend_from_slice(&196608i32.to_be_bytes());

            if let Some(username) = self.username {
                put_cstr(buf, "user");
                put_cstr(buf, username);
            }

            if let Some(database) = self.database {
                put_cstr(buf, "database");
                put_cstr(buf, database);
            }

            for (k, v) in self.params {
                put_cstr(buf, k);
                put_cstr(buf, v);
            }

            buf.push(0);
            Ok(())
        })
    }
}

pub enum Password<'a> {
    Cleartext(&'a str),
    Md5 {
        username: &'a str,
        password: &'a str,
        salt: [u8; 4],
    },
    /// Pre-built body (used for SASL initial-response / response messages,
    /// which reuse the `'p'` frontend format but carry an opaque payload).
    Raw(&'a [u8]),
}

impl FrontendMessage for Password<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        write_framed(buf, b'p', |buf| {
            match self {
                Password::Cleartext(password) => {
                    put_cstr(buf, password);
                }
                Password::Md5 {
                    username,
                    password,
                    salt,
                } => {
                    let hashed = crate::sasl::md5_password(username, password, salt);
                    put_cstr(buf, &hashed);
                }
                Password::Raw(bytes) => {
                    buf.extend_from_slice(bytes);
                }
            }
            Ok(())
        })
    }
}

pub struct Query<'a>(pub &'a str);

impl FrontendMessage for Query<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        write_framed(buf, b'Q', |buf| {
            put_cstr(buf, self.0);
            Ok(())
        })
    }
}

/// A single parameter's wire representation for `Bind`: text-encoded bytes,
/// or SQL `NULL`.
pub enum PgArgument<'a> {
    Text(&'a str),
    Null,
}

pub struct Parse<'a> {
    pub statement: &'a str,
    pub query: &'a str,
    pub param_types: &'a [u32],
}

impl FrontendMessage for Parse<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        let num_params = i16::try_from(self.param_types.len())
            .map_err(|_| crate::err_protocol!("too many parameters in one query"))?;
        write_framed(buf, b'P', |buf| {
            put_cstr(buf, self.statement);
            put_cstr(buf, self.query);
            buf.extend_from_slice(&num_params.to_be_bytes());
            for oid in self.param_types {
                buf.extend_from_slice(&oid.to_be_bytes());
            }
            Ok(())
        })
    }
}

pub struct Bind<'a> {
    pub portal: &'a str,
    pub statement: &'a str,
    pub params: &'a [PgArgument<'a>],
}

impl FrontendMessage for Bind<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        let num_params = i16::try_from(self.params.len())
            .map_err(|_| crate::err_protocol!("too many parameters in one query"))?;
        write_framed(buf, b'B', |buf| {
            put_cstr(buf, self.portal);
            put_cstr(buf, self.statement);

            // All parameters are sent in text format (format code 0).
            buf.extend_from_slice(&1i16.to_be_bytes());
            buf.extend_from_slice(&0i16.to_be_bytes());

            buf.extend_from_slice(&num_params.to_be_bytes());
            for param in self.params {
                match param {
                    PgArgument::Null => buf.extend_from_slice(&(-1i32).to_be_bytes()),
                    PgArgument::Text(value) => {
                        let len = i32::try_from(value.len()).map_err(|_| {
                            crate::err_protocol!("parameter value too large to encode")
                        })?;
                        buf.extend_from_slice(&len.to_be_bytes());
                        buf.extend_from_slice(value.as_bytes());
                    }
                }
            }

            // All results are requested in text format.
            buf.extend_from_slice(&1i16.to_be_bytes());
            buf.extend_from_slice(&0i16.to_be_bytes());
            Ok(())
        })
    }
}

pub enum Describe<'a> {
    Statement(&'a str),
    Portal(&'a str),
}

impl FrontendMessage for Describe<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        write_framed(buf, b'D', |buf| {
            match self {
                Describe::Statement(name) => {
                    buf.push(b'S');
                    put_cstr(buf, name);
                }
                Describe::Portal(name) => {
                    buf.push(b'P');
                    put_cstr(buf, name);
                }
            }
            Ok(())
        })
    }
}

pub struct Execute<'a> {
    pub portal: &'a str,
    pub limit: i32,
}

impl FrontendMessage for Execute<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        write_framed(buf, b'E', |buf| {
            put_cstr(buf, self.portal);
            buf.extend_from_slice(&self.limit.to_be_bytes());
            Ok(())
        })
    }
}

pub enum Close<'a> {
    Statement(&'a str),
    Portal(&'a str),
}

impl FrontendMessage for Close<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        write_framed(buf, b'C', |buf| {
            match self {
                Close::Statement(name) => {
                    buf.push(b'S');
                    put_cstr(buf, name);
                }
                Close::Portal(name) => {
                    buf.push(b'P');
                    put_cstr(buf, name);
                }
            }
            Ok(())
        })
    }
}

pub struct Sync;

impl FrontendMessage for Sync {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        write_framed(buf, b'S', |_| Ok(()))
    }
}

pub struct Terminate;

impl FrontendMessage for Terminate {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        write_framed(buf, b'X', |_| Ok(()))
    }
}

pub struct CopyData<'a>(pub &'a [u8]);

impl FrontendMessage for CopyData<'_> {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        write_framed(buf, b'd', |buf| {
            buf.extend_from_slice(self.0);
            Ok(())
        })
    }
}

pub struct CopyDone;

impl FrontendMessage for CopyDone {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        write_framed(buf, b'c', |_| Ok(()))
    }
}

pub struct CopyFail(String);

impl CopyFail {
    pub fn new(msg: impl Into<String>) -> Self {
        CopyFail(msg.into())
    }
}

impl FrontendMessage for CopyFail {
    fn encode(&self, buf: &mut Vec<u8>) -> crate::Result<()> {
        write_framed(buf, b'f', |buf| {
            put_cstr(buf, &self.0);
            Ok(())
        })
    }
}
