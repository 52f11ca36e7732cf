//! Payment challenges and their `WWW-Authenticate` encoding.
//!
//! A challenge is rendered as an `x402` authentication scheme with quoted
//! parameters:
//!
//! ```text
//! WWW-Authenticate: x402 scheme="exact", network="base-sepolia", amount="0.01",
//!     asset="0x036C...", payTo="0x742d...", resource="/api/unlock-box", description="..."
//! ```

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::{
    decision::ErrorReason,
    errors::{Error, Result},
    types::Price,
};

/// The authentication scheme name used in `WWW-Authenticate` and `Authorization`.
pub const AUTH_SCHEME: &str = "x402";

/// The only payment scheme Box3 issues.
pub const EXACT_SCHEME: &str = "exact";

/// Terms a client must satisfy to access a protected resource.
#[derive(Builder, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentChallenge {
    /// Payment scheme, e.g. `"exact"`.
    #[builder(into, default = EXACT_SCHEME.to_string())]
    pub scheme: String,
    /// Network identifier, e.g. `"base-sepolia"`.
    #[builder(into)]
    pub network: String,
    /// Amount as configured, echoed verbatim.
    #[builder(into)]
    pub amount: Price,
    /// Asset contract address or identifier.
    #[builder(into)]
    pub asset: String,
    /// Recipient address.
    #[builder(into)]
    pub pay_to: String,
    /// The protected resource path.
    #[builder(into)]
    pub resource: String,
    /// Human readable description.
    #[builder(into, default)]
    #[serde(default)]
    pub description: String,
}

impl PaymentChallenge {
    /// Whether every field a payer needs is present.
    pub fn is_complete(&self) -> bool {
        !self.scheme.is_empty()
            && !self.network.is_empty()
            && !self.amount.is_empty()
            && !self.asset.is_empty()
            && !self.pay_to.is_empty()
    }

    /// Render the `WWW-Authenticate` header value.
    pub fn to_www_authenticate(&self) -> String {
        let params = [
            ("scheme", self.scheme.as_str()),
            ("network", self.network.as_str()),
            ("amount", self.amount.as_str()),
            ("asset", self.asset.as_str()),
            ("payTo", self.pay_to.as_str()),
            ("resource", self.resource.as_str()),
            ("description", self.description.as_str()),
        ];

        let rendered = params
            .iter()
            .map(|(name, value)| format!("{name}=\"{}\"", quote(value)))
            .collect::<Vec<_>>()
            .join(", ");

        format!("{AUTH_SCHEME} {rendered}")
    }

    /// Parse a `WWW-Authenticate` header value.
    ///
    /// Unknown parameters are ignored; `resource` and `description` default to empty.
    pub fn from_www_authenticate(header: &str) -> Result<Self> {
        let header = header.trim();
        let (auth_scheme, rest) = header
            .split_once(char::is_whitespace)
            .unwrap_or((header, ""));
        if !auth_scheme.eq_ignore_ascii_case(AUTH_SCHEME) {
            return Err(Error::MalformedChallenge(format!(
                "unexpected auth scheme '{auth_scheme}'"
            )));
        }

        let mut scheme = None;
        let mut network = None;
        let mut amount = None;
        let mut asset = None;
        let mut pay_to = None;
        let mut resource = None;
        let mut description = None;

        for (name, value) in parse_params(rest)? {
            let slot = match name.as_str() {
                "scheme" => &mut scheme,
                "network" => &mut network,
                "amount" => &mut amount,
                "asset" => &mut asset,
                "payTo" => &mut pay_to,
                "resource" => &mut resource,
                "description" => &mut description,
                _ => continue,
            };
            *slot = Some(value);
        }

        let required = |field: Option<String>, name: &str| {
            field.ok_or_else(|| Error::MalformedChallenge(format!("missing parameter '{name}'")))
        };

        Ok(PaymentChallenge {
            scheme: required(scheme, "scheme")?,
            network: required(network, "network")?,
            amount: Price::new(required(amount, "amount")?),
            asset: required(asset, "asset")?,
            pay_to: required(pay_to, "payTo")?,
            resource: resource.unwrap_or_default(),
            description: description.unwrap_or_default(),
        })
    }
}

/// JSON body sent with every 402 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeBody {
    pub error: ErrorReason,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub challenge: Option<PaymentChallenge>,
}

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn parse_params(input: &str) -> Result<Vec<(String, String)>> {
    let mut params = Vec::new();
    let mut chars = input.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == ',').is_some() {}
        if chars.peek().is_none() {
            return Ok(params);
        }

        let mut name = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && *c != ',' && !c.is_whitespace()) {
            name.push(c);
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next() != Some('=') {
            return Err(Error::MalformedChallenge(format!(
                "parameter '{name}' has no value"
            )));
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        if chars.next_if_eq(&'"').is_some() {
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '\\' => {
                        if let Some(escaped) = chars.next() {
                            value.push(escaped);
                        }
                    }
                    '"' => {
                        closed = true;
                        break;
                    }
                    other => value.push(other),
                }
            }
            if !closed {
                return Err(Error::MalformedChallenge(format!(
                    "unterminated quoted value for '{name}'"
                )));
            }
        } else {
            while let Some(c) = chars.next_if(|c| *c != ',' && !c.is_whitespace()) {
                value.push(c);
            }
        }

        params.push((name, value));
    }
}
