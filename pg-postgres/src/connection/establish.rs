use crate::message::{Authentication, BackendKeyData, Password, ReadyForQuery, Startup};
use crate::options::PgConnectOptions;
use crate::sasl;

use super::stream::PgStream;
use super::PgConnection;

/// Run the startup/authentication handshake over a freshly connected
/// (and, if applicable, TLS-upgraded) socket and return a ready-to-use
/// connection sitting just past its first `ReadyForQuery`.
pub(crate) async fn establish(options: &PgConnectOptions) -> crate::Result<PgConnection> {
    let mut stream = PgStream::connect(options).await?;

    let mut params: Vec<(&str, &str)> = vec![
        ("client_encoding", "UTF8"),
        ("DateStyle", "ISO, MDY"),
        ("TimeZone", "UTC"),
    ];
    if let Some(extra) = &options.extra_float_digits {
        params.push(("extra_float_digits", extra));
    }
    if let Some(app_name) = &options.application_name {
        params.push(("application_name", app_name));
    }
    if let Some(opts) = &options.options {
        params.push(("options", opts));
    }

    stream
        .send(&Startup {
            username: Some(&options.username),
            database: options.database.as_deref(),
            params: &params,
        })
        .await?;

    authenticate(&mut stream, options).await?;

    let mut process_id = 0;
    let mut secret_key = 0;
    let transaction_status;

    loop {
        let message = stream.recv_message().await?;
        match message.format {
            crate::message::BackendMessageFormat::BackendKeyData => {
                let key_data: BackendKeyData = message.decode()?;
                process_id = key_data.process_id;
                secret_key = key_data.secret_key;
            }
            crate::message::BackendMessageFormat::ReadyForQuery => {
                let ready: ReadyForQuery = message.decode()?;
                transaction_status = ready.transaction_status;
                break;
            }
            other => {
                return Err(pg_core::err_protocol!(
                    "unexpected message during startup: {:?}",
                    other
                )
                .into())
            }
        }
    }

    Ok(PgConnection {
        stream,
        process_id,
        secret_key,
        transaction_status,
        transaction_depth: 0,
        dead: false,
    })
}

async fn authenticate(stream: &mut PgStream, options: &PgConnectOptions) -> crate::Result<()> {
    let auth: Authentication = stream.recv_expect().await?;

    match auth {
        Authentication::Ok => Ok(()),
        Authentication::CleartextPassword => {
            let password = options.password.as_deref().ok_or_else(|| {
                crate::Error::AuthFailed("server requires a password but none was provided".into())
            })?;
            stream.send(&Password::Cleartext(password)).await?;
            expect_auth_ok(stream).await
        }
        Authentication::Md5Password(body) => {
            let password = options.password.as_deref().ok_or_else(|| {
                crate::Error::AuthFailed("server requires a password but none was provided".into())
            })?;
            stream
                .send(&Password::Md5 {
                    username: &options.username,
                    password,
                    salt: body.salt,
                })
                .await?;
            expect_auth_ok(stream).await
        }
        Authentication::Sasl(body) => {
            let password = options.password.as_deref().ok_or_else(|| {
                crate::Error::AuthFailed("server requires a password but none was provided".into())
            })?;

            sasl::authenticate(body, password, |payload| {
                let stream = &mut *stream;
                async move {
                    stream.send(&Password::Raw(&payload)).await?;
                    stream.recv_expect::<Authentication>().await
                }
            })
            .await?;

            expect_auth_ok(stream).await
        }
        other => Err(crate::Error::AuthFailed(format!(
            "unexpected authentication message: {other:?}"
        ))),
    }
}

async fn expect_auth_ok(stream: &mut PgStream) -> crate::Result<()> {
    match stream.recv_expect::<Authentication>().await? {
        Authentication::Ok => Ok(()),
        other => Err(crate::Error::AuthFailed(format!(
            "expected AuthenticationOk, got {other:?}"
        ))),
    }
}
