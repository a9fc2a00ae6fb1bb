//! HTTP Signatures (draft-cavage, hs2019 and rsa-sha256) verification

use std::collections::BTreeMap;
use std::iter::Peekable;
use std::str::Chars;

use anyhow::{Result, bail};
use aws_lc_rs::signature::{
    ECDSA_P256_SHA256_ASN1, ECDSA_P256_SHA256_FIXED, ECDSA_P256K1_SHA256_ASN1,
    ECDSA_P256K1_SHA256_FIXED, ED25519, RSA_PKCS1_2048_8192_SHA256, RSA_PSS_2048_8192_SHA256,
    UnparsedPublicKey, VerificationAlgorithm,
};
use base64ct::{Base64, Encoding};
use const_oid::db::rfc5912::{ID_EC_PUBLIC_KEY, RSA_ENCRYPTION};
use const_oid::db::rfc8410::ID_ED_25519;
use sha2::{Digest, Sha256, Sha512};
use spki::SubjectPublicKeyInfoRef;
use tracing::warn;

use crate::activity_pub::InboxError;
use crate::activity_pub::message::RequestContext;

/// Parsed `Signature` header of an inbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct HttpSignature {
    pub(crate) key_id: String,
    headers: Vec<String>,
    created: Option<String>,
    expires: Option<String>,
    signature: Vec<u8>,
}

impl HttpSignature {
    pub(crate) fn from_request(request: &RequestContext) -> Result<HttpSignature> {
        let header = request
            .header("signature")
            .ok_or_else(|| invalid("missing signature header"))?;
        let mut params = parse_sig_params(header).map_err(|e| invalid(e.to_string()))?;
        if let Some(algorithm) = params.get("algorithm") {
            if !["hs2019", "rsa-sha256"].contains(&algorithm.as_str()) {
                warn!(
                    target: "sig",
                    "unknown http signature algorithm {algorithm} used, verification will likely fail"
                );
            }
        }
        let signature = params
            .get("signature")
            .ok_or_else(|| invalid("missing signature param"))?;
        let signature = Base64::decode_vec(signature).map_err(|e| invalid(e.to_string()))?;
        // without a headers param only `date` is signed
        let headers = match params.get("headers") {
            Some(headers) => parse_headers(headers).map_err(|e| invalid(e.to_string()))?,
            None => vec!["date".to_string()],
        };
        let key_id = params
            .remove("keyId")
            .ok_or_else(|| invalid("missing keyId param"))?;
        Ok(HttpSignature {
            key_id,
            headers,
            created: params.remove("created"),
            expires: params.remove("expires"),
            signature,
        })
    }

    /// IRI of the actor owning the key.
    pub(crate) fn signer(&self) -> &str {
        self.key_id
            .split_once('#')
            .map_or(self.key_id.as_str(), |(owner, _)| owner)
    }

    pub(crate) fn check_expiry(&self, now: i64) -> Result<()> {
        let Some(expires) = &self.expires else {
            return Ok(());
        };
        let expires: f64 = expires
            .parse()
            .map_err(|_| invalid(format!("invalid expires param {expires}")))?;
        if expires < now as f64 {
            return Err(invalid("signature expired").into());
        }
        Ok(())
    }

    /// The string the remote signed, rebuilt from `request` and `body`.
    /// A non-empty body must be covered through a signed `digest`.
    pub(crate) fn signing_string(&self, request: &RequestContext, body: &[u8]) -> Result<String> {
        if !body.is_empty() && !self.headers.iter().any(|header| header == "digest") {
            bail!(invalid("request body is not covered by the signature"));
        }
        signing_string(&self.headers, self.created.as_deref(), self.expires.as_deref(), request, body)
    }

    pub(crate) fn verify(&self, public_key_pem: &str, signing_string: &str) -> Result<bool> {
        verify_pem(public_key_pem, signing_string.as_bytes(), &self.signature)
    }
}

fn invalid(reason: impl Into<String>) -> InboxError {
    InboxError::InvalidSignature(reason.into())
}

fn signing_string(
    headers: &[String],
    created: Option<&str>,
    expires: Option<&str>,
    request: &RequestContext,
    body: &[u8],
) -> Result<String> {
    let mut lines = Vec::with_capacity(headers.len());
    for header in headers {
        match header.as_str() {
            "(request-target)" => {
                let method = request.method.to_ascii_lowercase();
                lines.push(format!("(request-target): {method} {}", request.path));
            }
            "(created)" => {
                let created = created.ok_or_else(|| invalid("missing created param"))?;
                lines.push(format!("(created): {created}"));
            }
            "(expires)" => {
                let expires = expires.ok_or_else(|| invalid("missing expires param"))?;
                lines.push(format!("(expires): {expires}"));
            }
            "digest" => {
                let client_digest = request
                    .header("digest")
                    .ok_or_else(|| invalid("missing digest header"))?;
                let (alg, _) = client_digest
                    .split_once('=')
                    .ok_or_else(|| invalid("malformed digest header"))?;
                let digest = match alg.to_ascii_uppercase().as_str() {
                    "SHA-256" => base64_sha256_string(body),
                    "SHA-512" => base64_sha512_string(body),
                    _ => bail!(invalid(format!("unsupported digest {alg}"))),
                };
                lines.push(format!("digest: {alg}={digest}"));
            }
            field => {
                let value = request
                    .header(field)
                    .ok_or_else(|| invalid(format!("missing signed header {field}")))?;
                lines.push(format!("{field}: {value}"));
            }
        }
    }
    Ok(lines.join("\n"))
}

fn verify_pem(public_key_pem: &str, message: &[u8], signature: &[u8]) -> Result<bool> {
    let (label, der) = pem_rfc7468::decode_vec(public_key_pem.as_bytes())
        .map_err(|e| invalid(format!("invalid public key pem: {e}")))?;
    if label != "PUBLIC KEY" {
        bail!(invalid(format!("unsupported key type {label}")));
    }

    let spki = SubjectPublicKeyInfoRef::try_from(der.as_ref())
        .map_err(|e| invalid(format!("invalid public key: {e}")))?;
    let spk = spki
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| invalid("public key is not octet aligned"))?;

    let algorithms: &[&'static dyn VerificationAlgorithm] = match spki.algorithm.oid {
        RSA_ENCRYPTION => &[
            &RSA_PSS_2048_8192_SHA256 as &dyn VerificationAlgorithm,
            &RSA_PKCS1_2048_8192_SHA256 as &dyn VerificationAlgorithm,
        ],
        ID_ED_25519 => &[&ED25519 as &dyn VerificationAlgorithm],
        ID_EC_PUBLIC_KEY => &[
            &ECDSA_P256_SHA256_FIXED as &dyn VerificationAlgorithm,
            &ECDSA_P256K1_SHA256_FIXED as &dyn VerificationAlgorithm,
            &ECDSA_P256_SHA256_ASN1 as &dyn VerificationAlgorithm,
            &ECDSA_P256K1_SHA256_ASN1 as &dyn VerificationAlgorithm,
        ],
        oid => bail!(invalid(format!("unsupported key algorithm {oid}"))),
    };
    Ok(algorithms.iter().any(|&alg| {
        UnparsedPublicKey::new(alg, spk)
            .verify(message, signature)
            .is_ok()
    }))
}

pub(crate) fn base64_sha256_string(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    Base64::encode_string(hasher.finalize().as_slice())
}

fn base64_sha512_string(bytes: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(bytes);
    Base64::encode_string(hasher.finalize().as_slice())
}

fn parse_sig_params(input: &str) -> Result<BTreeMap<String, String>> {
    let mut params = BTreeMap::new();
    let mut it = input.chars().peekable();
    while it.peek().is_some() {
        eat_bws(&mut it);
        let token = eat_token(&mut it)?;
        eat_bws(&mut it);
        eat_eq(&mut it)?;
        eat_bws(&mut it);
        let value = if it.peek() == Some(&'"') {
            eat_quoted_string(&mut it)?
        } else {
            eat_token(&mut it)?
        };
        params.insert(token, value);
        eat_bws(&mut it);
        if it.peek().is_none() {
            break;
        }
        eat_comma(&mut it)?;
        eat_bws(&mut it);
    }
    Ok(params)
}

fn parse_headers(input: &str) -> Result<Vec<String>> {
    let mut headers = vec![];
    let mut it = input.chars().peekable();
    while it.peek().is_some() {
        eat_bws(&mut it);
        let header = eat_string(&mut it)?;
        headers.push(header.to_ascii_lowercase());
        eat_bws(&mut it);
    }
    Ok(headers)
}

fn eat_bws(it: &mut Peekable<Chars<'_>>) {
    while it.next_if(char::is_ascii_whitespace).is_some() {}
}
fn eat_eq(it: &mut Peekable<Chars<'_>>) -> Result<()> {
    if it.next_if_eq(&'=').is_none() {
        bail!("invalid auth-param, missing expected '='");
    }
    Ok(())
}
fn eat_comma(it: &mut Peekable<Chars<'_>>) -> Result<()> {
    if it.next_if_eq(&',').is_none() {
        bail!("invalid auth-param, missing expected ','");
    }
    Ok(())
}
#[rustfmt::skip]
fn is_tchar(c: &char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(c, '!'| '#'| '$'| '%'| '&'| '\''| '*'| '+'| '-'| '.'| '^'| '_'| '`'| '|'| '~')
}
fn eat_token(it: &mut Peekable<Chars<'_>>) -> Result<String> {
    let mut token = String::new();
    while let Some(c) = it.next_if(is_tchar) {
        token.push(c);
    }
    if token.is_empty() {
        bail!("expected at least one tchar");
    }
    Ok(token)
}
fn eat_string(it: &mut Peekable<Chars<'_>>) -> Result<String> {
    let mut token = String::new();
    while let Some(c) = it.next_if(|c| !c.is_ascii_whitespace()) {
        token.push(c);
    }
    if token.is_empty() {
        bail!("expected at least one char");
    }
    Ok(token)
}
fn eat_quoted_string(it: &mut Peekable<Chars<'_>>) -> Result<String> {
    let mut string = String::new();
    if it.next_if_eq(&'"').is_none() {
        bail!("expected DQUOTE");
    }
    let mut has_right_dquote = false;
    while let Some(c) = it.next() {
        // quoted-pair
        if c == '\\' {
            if it.next_if_eq(&'"').is_some() {
                string.push('"');
            }
            continue;
        }
        if c == '"' {
            has_right_dquote = true;
            break;
        }
        string.push(c);
    }
    if !has_right_dquote {
        bail!("expected a pair of DQUOTE");
    }
    Ok(string)
}

#[cfg(test)]
pub(crate) mod tests {
    use aws_lc_rs::encoding::AsDer;
    use aws_lc_rs::signature::{Ed25519KeyPair, KeyPair as _};
    use base64ct::{Base64, Encoding};

    use super::{
        HttpSignature, base64_sha256_string, parse_headers, parse_sig_params, signing_string,
    };
    use crate::activity_pub::message::RequestContext;

    /// Ed25519 signer producing requests the way remote servers do.
    pub(crate) struct TestSigner {
        key_pair: Ed25519KeyPair,
        pub(crate) public_key_pem: String,
    }

    impl TestSigner {
        pub(crate) fn new() -> TestSigner {
            let key_pair = Ed25519KeyPair::generate().unwrap();
            let public_key = key_pair.public_key().as_der().unwrap();
            let public_key_pem = pem_rfc7468::encode_string(
                "PUBLIC KEY",
                pem_rfc7468::LineEnding::LF,
                public_key.as_ref(),
            )
            .unwrap();
            TestSigner {
                key_pair,
                public_key_pem,
            }
        }

        pub(crate) fn sign(&self, key_id: &str, body: &str) -> RequestContext {
            self.sign_headers(key_id, body, "(request-target) host date digest")
        }

        pub(crate) fn sign_headers(&self, key_id: &str, body: &str, signed: &str) -> RequestContext {
            let mut request = RequestContext {
                method: "POST".to_string(),
                path: "/inbox".to_string(),
                headers: vec![
                    ("Host".to_string(), "kiosk.example".to_string()),
                    ("Date".to_string(), "Tue, 07 Jun 2022 20:51:35 GMT".to_string()),
                    (
                        "Digest".to_string(),
                        format!("SHA-256={}", base64_sha256_string(body.as_bytes())),
                    ),
                ],
            };
            let headers = parse_headers(signed).unwrap();
            let message = signing_string(&headers, None, None, &request, body.as_bytes()).unwrap();
            let signature = Base64::encode_string(self.key_pair.sign(message.as_bytes()).as_ref());
            request.headers.push((
                "Signature".to_string(),
                format!(
                    "keyId=\"{key_id}\",algorithm=\"hs2019\",headers=\"{signed}\",signature=\"{signature}\""
                ),
            ));
            request
        }
    }

    #[test]
    fn test_parse_sig_params() {
        let signature = r#"keyId="id=\\"123\\"",algorithm="hs2019",
            created=1402170695, expires=1402170995,
            headers="(request-target) (created) (expires)
               host date digest content-length",
            signature="6QQ1ckyr6Tge+t0sBe99S3qyMjW6AF6kLeL7bV6ByzM=""#;
        let params = parse_sig_params(signature).unwrap();

        assert_eq!(params.get("keyId"), Some(&"id=\"123\"".to_string()));
        assert_eq!(params.get("algorithm"), Some(&"hs2019".to_string()));
        assert_eq!(params.get("created"), Some(&"1402170695".to_string()));
        assert_eq!(params.get("expires"), Some(&"1402170995".to_string()));
        assert_eq!(
            params.get("signature"),
            Some(&"6QQ1ckyr6Tge+t0sBe99S3qyMjW6AF6kLeL7bV6ByzM=".to_string())
        );
    }

    #[test]
    fn test_parse_headers() {
        let input =
            "(request-target) (created) (expires)\n               host date digest content-length";
        let headers = parse_headers(input).unwrap();
        assert_eq!(
            headers,
            vec![
                "(request-target)",
                "(created)",
                "(expires)",
                "host",
                "date",
                "digest",
                "content-length"
            ]
        );
    }

    #[test]
    fn signed_request_verifies() {
        let signer = TestSigner::new();
        let body = r#"{"type":"Like"}"#;
        let request = signer.sign("https://remote.example/u/alice#main-key", body);

        let signature = HttpSignature::from_request(&request).unwrap();
        assert_eq!(signature.signer(), "https://remote.example/u/alice");
        let message = signature.signing_string(&request, body.as_bytes()).unwrap();
        assert!(message.starts_with("(request-target): post /inbox\nhost: kiosk.example"));
        assert!(signature.verify(&signer.public_key_pem, &message).unwrap());

        // tampered body no longer matches the signed digest
        let message = signature
            .signing_string(&request, br#"{"type":"Dislike"}"#)
            .unwrap();
        assert!(!signature.verify(&signer.public_key_pem, &message).unwrap());

        // a different key does not verify
        let other = TestSigner::new();
        let message = signature.signing_string(&request, body.as_bytes()).unwrap();
        assert!(!signature.verify(&other.public_key_pem, &message).unwrap());
    }

    #[test]
    fn unsigned_body_is_rejected() {
        let signer = TestSigner::new();
        let body = r#"{"type":"Like"}"#;
        let request = signer.sign_headers(
            "https://remote.example/u/alice#main-key",
            body,
            "(request-target) host date",
        );
        let signature = HttpSignature::from_request(&request).unwrap();
        let error = signature
            .signing_string(&request, body.as_bytes())
            .unwrap_err();
        assert_eq!(
            crate::activity_pub::classify(&error),
            crate::activity_pub::Disposition::Drop
        );
        // nothing to cover without a body
        assert!(signature.signing_string(&request, b"").is_ok());
    }

    #[test]
    fn malformed_key_is_an_invalid_signature() {
        let signer = TestSigner::new();
        let request = signer.sign("https://remote.example/u/alice#main-key", "{}");
        let signature = HttpSignature::from_request(&request).unwrap();
        let message = signature.signing_string(&request, b"{}").unwrap();
        let error = signature.verify("not a pem", &message).unwrap_err();
        assert_eq!(
            crate::activity_pub::classify(&error),
            crate::activity_pub::Disposition::Drop
        );
    }

    #[test]
    fn expired_signature_is_rejected() {
        let request = RequestContext {
            method: "POST".to_string(),
            path: "/inbox".to_string(),
            headers: vec![(
                "Signature".to_string(),
                r#"keyId="https://remote.example/u/a#k",headers="(expires)",expires=1402170995,signature="AAAA""#
                    .to_string(),
            )],
        };
        let signature = HttpSignature::from_request(&request).unwrap();
        assert!(signature.check_expiry(1402170000).is_ok());
        assert!(signature.check_expiry(1402171000).is_err());
    }

    #[test]
    fn missing_signature_header_is_invalid() {
        let request = RequestContext {
            method: "POST".to_string(),
            path: "/inbox".to_string(),
            headers: vec![],
        };
        let error = HttpSignature::from_request(&request).unwrap_err();
        assert_eq!(
            crate::activity_pub::classify(&error),
            crate::activity_pub::Disposition::Drop
        );
    }
}
