//! Wire flavor codes.
//!
//! A [`Flavor`] is the negotiated tuple of policy, mechanism, service
//! class, and bulk service that every RPC carries. It packs into a single
//! `u32` so that flavor comparisons across the wire are a plain integer
//! compare — this is what the design means by "equality is byte-wise over
//! the full flavor struct".
//!
//! Bit layout (low to high): mechanism\[0..8\], policy number\[8..16\],
//! service class\[16..18\], bulk service\[18..20\], hash algorithm
//! (plain only)\[20..24\], reverse flag\[24\], root-only flag\[25\]. This
//! layout is our own choice — the upstream bit layout lived in a header
//! that wasn't part of the retrieved source — but it preserves every
//! invariant the spec requires: byte-wise equality, a policy number
//! extractable without decoding the rest, and independent service/bulk
//! sub-fields.

use std::fmt;

use crate::error::{SecError, SecResult};

const MECH_SHIFT: u32 = 0;
const MECH_MASK: u32 = 0xFF;
const POLICY_SHIFT: u32 = 8;
const POLICY_MASK: u32 = 0xFF;
const SVC_SHIFT: u32 = 16;
const SVC_MASK: u32 = 0b11;
const BULK_SHIFT: u32 = 18;
const BULK_MASK: u32 = 0b11;
const HASH_SHIFT: u32 = 20;
const HASH_MASK: u32 = 0xF;
const REVERSE_BIT: u32 = 1 << 24;
const ROOTONLY_BIT: u32 = 1 << 25;

/// Wire-policy numbers for the base flavors this crate knows how to name.
/// Real deployments register additional policies (e.g. GSS mechanisms)
/// under their own numbers; these four are just the ones spec §6 requires
/// us to be able to parse and print by name.
pub mod policy_numbers {
    /// The null policy: no transformation at all.
    pub const NULL: u16 = 0;
    /// The plain policy: a checksum-only mechanism, no encryption.
    pub const PLAIN: u16 = 1;
    /// A GSS-backed policy family (e.g. Kerberos 5).
    pub const GSS: u16 = 2;
    /// A shared-key policy family.
    pub const SHARED_KEY: u16 = 3;
}

const MECH_NONE: u32 = 0;
const MECH_KRB5: u32 = 1;

/// The service class negotiated for a flavor: how much protection the RPC
/// body gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceClass {
    /// No transformation; the body travels as plaintext with no MIC.
    Null,
    /// Authentication only: the caller's identity is attested, the body
    /// is not protected.
    Auth,
    /// Integrity: the body is signed (a MIC is attached) but not
    /// encrypted.
    Integrity,
    /// Privacy: the body is encrypted (sealed).
    Privacy,
}

impl ServiceClass {
    fn from_bits(bits: u32) -> Self {
        match bits {
            0 => Self::Null,
            1 => Self::Auth,
            2 => Self::Integrity,
            _ => Self::Privacy,
        }
    }

    fn to_bits(self) -> u32 {
        match self {
            Self::Null => 0,
            Self::Auth => 1,
            Self::Integrity => 2,
            Self::Privacy => 3,
        }
    }
}

/// The bulk-data service class, tracked independently of the RPC body's
/// [`ServiceClass`] because bulk I/O is protected (or not) on its own
/// schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BulkService {
    /// Bulk payload is not protected.
    Null,
    /// Bulk payload is checksummed.
    Integrity,
    /// Bulk payload is encrypted.
    Privacy,
}

impl BulkService {
    fn from_bits(bits: u32) -> Self {
        match bits {
            0 => Self::Null,
            1 => Self::Integrity,
            _ => Self::Privacy,
        }
    }

    fn to_bits(self) -> u32 {
        match self {
            Self::Null => 0,
            Self::Integrity => 1,
            Self::Privacy => 2,
        }
    }

    /// Whether this bulk service counts as "bulk-protected" for flavor
    /// policy purposes. Per spec §6, only `intg` and `priv` count.
    #[must_use]
    pub fn is_protected(self) -> bool {
        !matches!(self, Self::Null)
    }
}

/// The checksum algorithm a `plain` flavor uses for its bulk hash
/// sub-specifier (`plain-hash:<name>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlg {
    /// No hash sub-specifier was given; the mechanism's default applies.
    Default,
    /// SHA-256.
    Sha256,
    /// SHA-1.
    Sha1,
    /// Adler-32 (fast, weak — legacy compatibility only).
    Adler32,
    /// CRC-32.
    Crc32,
}

impl HashAlg {
    fn from_bits(bits: u32) -> Self {
        match bits {
            1 => Self::Sha256,
            2 => Self::Sha1,
            3 => Self::Adler32,
            4 => Self::Crc32,
            _ => Self::Default,
        }
    }

    fn to_bits(self) -> u32 {
        match self {
            Self::Default => 0,
            Self::Sha256 => 1,
            Self::Sha1 => 2,
            Self::Adler32 => 3,
            Self::Crc32 => 4,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Sha256 => "sha256",
            Self::Sha1 => "sha1",
            Self::Adler32 => "adler32",
            Self::Crc32 => "crc32",
        }
    }

    fn parse(s: &str) -> SecResult<Self> {
        match s {
            "default" => Ok(Self::Default),
            "sha256" => Ok(Self::Sha256),
            "sha1" => Ok(Self::Sha1),
            "adler32" => Ok(Self::Adler32),
            "crc32" => Ok(Self::Crc32),
            other => Err(SecError::InvalidFlavorName(format!(
                "unknown hash algorithm: {other}"
            ))),
        }
    }
}

/// Which side of the connection a [`Sec`](../fsrpc_sec/struct.Sec.html)
/// plays: the requesting client, or the server building a reverse
/// security instance to talk back to a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Part {
    /// Ordinary client-side role.
    Client,
    /// Server-side role, importing back to a client (reverse sec).
    Server,
}

/// A negotiated RPC flavor: policy, mechanism, service class, and bulk
/// service packed into a single comparable value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Flavor {
    rpc: u32,
}

impl Flavor {
    fn from_parts(
        policy: u16,
        mechanism: u32,
        svc: ServiceClass,
        bulk: BulkService,
        hash: HashAlg,
    ) -> Self {
        let rpc = ((mechanism & MECH_MASK) << MECH_SHIFT)
            | ((u32::from(policy) & POLICY_MASK) << POLICY_SHIFT)
            | ((svc.to_bits() & SVC_MASK) << SVC_SHIFT)
            | ((bulk.to_bits() & BULK_MASK) << BULK_SHIFT)
            | ((hash.to_bits() & HASH_MASK) << HASH_SHIFT);
        Self { rpc }
    }

    /// Build the flavor from its already-packed wire representation.
    #[must_use]
    pub const fn from_wire(rpc: u32) -> Self {
        Self { rpc }
    }

    /// The packed wire representation, suitable for placing directly into
    /// an outgoing `lustre_msg`-equivalent header.
    #[must_use]
    pub const fn wire(self) -> u32 {
        self.rpc
    }

    /// The wire-policy number this flavor is bound to.
    #[must_use]
    pub fn policy_number(self) -> u16 {
        ((self.rpc >> POLICY_SHIFT) & POLICY_MASK) as u16
    }

    /// The service class negotiated for the RPC body.
    #[must_use]
    pub fn service(self) -> ServiceClass {
        ServiceClass::from_bits((self.rpc >> SVC_SHIFT) & SVC_MASK)
    }

    /// The bulk service class.
    #[must_use]
    pub fn bulk_service(self) -> BulkService {
        BulkService::from_bits((self.rpc >> BULK_SHIFT) & BULK_MASK)
    }

    /// The plain-policy hash sub-specifier, if any.
    #[must_use]
    pub fn hash_alg(self) -> HashAlg {
        HashAlg::from_bits((self.rpc >> HASH_SHIFT) & HASH_MASK)
    }

    /// Whether the `REVERSE` flag is set (this flavor belongs to a
    /// reverse `Sec`).
    #[must_use]
    pub const fn is_reverse(self) -> bool {
        self.rpc & REVERSE_BIT != 0
    }

    /// Whether the `ROOTONLY` flag is set.
    #[must_use]
    pub const fn is_root_only(self) -> bool {
        self.rpc & ROOTONLY_BIT != 0
    }

    /// Return this flavor with the `REVERSE | ROOTONLY` bits forced on,
    /// as `Sec::create` does for a server-side reverse sec (spec §4.B).
    #[must_use]
    pub const fn as_reverse(self) -> Self {
        Self {
            rpc: self.rpc | REVERSE_BIT | ROOTONLY_BIT,
        }
    }

    /// This flavor with the reverse/root-only flag bits cleared, for
    /// comparisons that should ignore role.
    #[must_use]
    pub const fn base(self) -> Self {
        Self {
            rpc: self.rpc & !(REVERSE_BIT | ROOTONLY_BIT),
        }
    }

    /// The null flavor: no policy, no protection.
    #[must_use]
    pub fn null() -> Self {
        Self::from_parts(
            policy_numbers::NULL,
            MECH_NONE,
            ServiceClass::Null,
            BulkService::Null,
            HashAlg::Default,
        )
    }

    /// The plain flavor with an optional bulk-hash sub-specifier.
    #[must_use]
    pub fn plain(hash: HashAlg) -> Self {
        Self::from_parts(
            policy_numbers::PLAIN,
            MECH_NONE,
            ServiceClass::Auth,
            BulkService::Null,
            hash,
        )
    }

    fn gss(mechanism: u32, svc: ServiceClass) -> Self {
        let bulk = match svc {
            ServiceClass::Integrity => BulkService::Integrity,
            ServiceClass::Privacy => BulkService::Privacy,
            _ => BulkService::Null,
        };
        Self::from_parts(policy_numbers::GSS, mechanism, svc, bulk, HashAlg::Default)
    }

    fn shared_key(svc: ServiceClass) -> Self {
        let bulk = match svc {
            ServiceClass::Integrity => BulkService::Integrity,
            ServiceClass::Privacy => BulkService::Privacy,
            _ => BulkService::Null,
        };
        Self::from_parts(
            policy_numbers::SHARED_KEY,
            MECH_NONE,
            svc,
            bulk,
            HashAlg::Default,
        )
    }

    /// Parse one of the named base flavors (`null`, `plain`, `gssnull`,
    /// `krb5n`, `krb5a`, `krb5i`, `krb5p`, `skn`, `ska`, `ski`, `skpi`),
    /// optionally with a trailing `-hash:<name>` sub-specifier on
    /// `plain`. Any other string is [`SecError::InvalidFlavorName`].
    pub fn parse(name: &str) -> SecResult<Self> {
        if let Some(rest) = name.strip_prefix("plain-hash:") {
            return Ok(Self::plain(HashAlg::parse(rest)?));
        }

        match name {
            "null" => Ok(Self::null()),
            "plain" => Ok(Self::plain(HashAlg::Default)),
            "gssnull" => Ok(Self::gss(MECH_NONE, ServiceClass::Null)),
            "krb5n" => Ok(Self::gss(MECH_KRB5, ServiceClass::Null)),
            "krb5a" => Ok(Self::gss(MECH_KRB5, ServiceClass::Auth)),
            "krb5i" => Ok(Self::gss(MECH_KRB5, ServiceClass::Integrity)),
            "krb5p" => Ok(Self::gss(MECH_KRB5, ServiceClass::Privacy)),
            "skn" => Ok(Self::shared_key(ServiceClass::Null)),
            "ska" => Ok(Self::shared_key(ServiceClass::Auth)),
            "ski" => Ok(Self::shared_key(ServiceClass::Integrity)),
            "skpi" => Ok(Self::shared_key(ServiceClass::Privacy)),
            other => Err(SecError::InvalidFlavorName(other.to_string())),
        }
    }

    /// The base name for this flavor (without any `-hash:` suffix),
    /// the inverse of [`Flavor::parse`] modulo the hash sub-specifier.
    #[must_use]
    pub fn base_name(self) -> &'static str {
        let base = self.base();
        match (base.policy_number(), base.mechanism(), base.service()) {
            (p, _, _) if p == policy_numbers::NULL => "null",
            (p, _, _) if p == policy_numbers::PLAIN => "plain",
            (p, MECH_NONE, ServiceClass::Null) if p == policy_numbers::GSS => "gssnull",
            (p, MECH_KRB5, ServiceClass::Null) if p == policy_numbers::GSS => "krb5n",
            (p, MECH_KRB5, ServiceClass::Auth) if p == policy_numbers::GSS => "krb5a",
            (p, MECH_KRB5, ServiceClass::Integrity) if p == policy_numbers::GSS => "krb5i",
            (p, MECH_KRB5, ServiceClass::Privacy) if p == policy_numbers::GSS => "krb5p",
            (p, _, ServiceClass::Null) if p == policy_numbers::SHARED_KEY => "skn",
            (p, _, ServiceClass::Auth) if p == policy_numbers::SHARED_KEY => "ska",
            (p, _, ServiceClass::Integrity) if p == policy_numbers::SHARED_KEY => "ski",
            (p, _, ServiceClass::Privacy) if p == policy_numbers::SHARED_KEY => "skpi",
            _ => "invalid",
        }
    }

    /// The full name, including the `-hash:<name>` suffix for plain
    /// flavors carrying a non-default hash.
    #[must_use]
    pub fn name(self) -> String {
        if self.base().policy_number() == policy_numbers::PLAIN
            && self.hash_alg() != HashAlg::Default
        {
            format!("plain-hash:{}", self.hash_alg().name())
        } else {
            self.base_name().to_string()
        }
    }

    fn mechanism(self) -> u32 {
        (self.rpc >> MECH_SHIFT) & MECH_MASK
    }

    /// Whether `other`'s flavor is acceptable in place of `self`
    /// (typically: the export's configured flavor compared against an
    /// incoming request's flavor). Mirrors `flavor_allowed` from the
    /// flavor-gate logic: an exact match is always allowed; during
    /// context init/fini the policy+mechanism pair is enough even if the
    /// service class differs, since the init exchange itself negotiates
    /// the service class.
    #[must_use]
    pub fn accepts(self, other: Self, is_ctx_negotiation: bool) -> bool {
        if self.base() == other.base() {
            return true;
        }
        is_ctx_negotiation
            && self.policy_number() == other.policy_number()
            && self.mechanism() == other.mechanism()
    }
}

impl fmt::Debug for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flavor({:#010x}, {})", self.rpc, self.name())
    }
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NAMED_BASE_FLAVORS: &[&str] = &[
        "null", "plain", "gssnull", "krb5n", "krb5a", "krb5i", "krb5p", "skn", "ska", "ski",
        "skpi",
    ];

    #[test]
    fn flavor_round_trip_for_every_named_base() {
        for name in NAMED_BASE_FLAVORS {
            let flavor = Flavor::parse(name).unwrap();
            assert_eq!(flavor.base_name(), *name, "round trip failed for {name}");
        }
    }

    #[test]
    fn plain_hash_round_trips_through_name() {
        let flavor = Flavor::parse("plain-hash:sha256").unwrap();
        assert_eq!(flavor.hash_alg(), HashAlg::Sha256);
        assert_eq!(flavor.name(), "plain-hash:sha256");
    }

    #[test]
    fn unknown_name_is_invalid() {
        assert!(matches!(
            Flavor::parse("bogus"),
            Err(SecError::InvalidFlavorName(_))
        ));
    }

    #[test]
    fn equality_ignores_nothing_byte_wise() {
        let a = Flavor::parse("krb5i").unwrap();
        let b = Flavor::parse("krb5i").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.wire(), b.wire());
    }

    #[test]
    fn reverse_root_only_bits_round_trip() {
        let base = Flavor::parse("krb5i").unwrap();
        let reverse = base.as_reverse();
        assert!(reverse.is_reverse());
        assert!(reverse.is_root_only());
        assert_eq!(reverse.base(), base);
        assert_ne!(reverse, base);
    }

    #[test]
    fn bulk_service_protection_matches_spec() {
        assert!(!BulkService::Null.is_protected());
        assert!(BulkService::Integrity.is_protected());
        assert!(BulkService::Privacy.is_protected());
    }

    #[test]
    fn krb5_bulk_mirrors_service_class() {
        let i = Flavor::parse("krb5i").unwrap();
        let p = Flavor::parse("krb5p").unwrap();
        assert_eq!(i.bulk_service(), BulkService::Integrity);
        assert_eq!(p.bulk_service(), BulkService::Privacy);
    }

    #[test]
    fn accepts_exact_match() {
        let f = Flavor::parse("ska").unwrap();
        assert!(f.accepts(f, false));
    }

    #[test]
    fn accepts_ctx_negotiation_relaxes_service_class() {
        let configured = Flavor::parse("krb5i").unwrap();
        let init_req = Flavor::parse("krb5n").unwrap();
        assert!(!configured.accepts(init_req, false));
        assert!(configured.accepts(init_req, true));
    }

    #[test]
    fn accepts_rejects_cross_mechanism_even_during_negotiation() {
        let configured = Flavor::parse("krb5i").unwrap();
        let other = Flavor::parse("ski").unwrap();
        assert!(!configured.accepts(other, true));
    }
}
