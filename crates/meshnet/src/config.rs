//! Proxy tuning params.

use crate::timeout::ProxyTimeout;

/// Home of the plain [`tuning_params_struct::ProxyTuningParams`] struct.
/// Code passes the shared [`ProxyTuningParams`] alias around instead.
pub mod tuning_params_struct {
    use std::collections::HashMap;

    macro_rules! mk_tune {
        ($($(#[doc = $doc:expr])* $i:ident: $t:ty = $d:expr,)*) => {
            /// Knobs for proxy timing and leases.
            ///
            /// Every value travels as a string. Unknown keys and values that
            /// do not parse are logged and skipped, so a config written for
            /// another version still loads.
            #[non_exhaustive]
            #[derive(Clone, Debug, PartialEq)]
            pub struct ProxyTuningParams {
                $(
                    $(#[doc = $doc])*
                    pub $i: $t,
                )*
            }

            impl Default for ProxyTuningParams {
                fn default() -> Self {
                    Self {
                        $(
                            $i: $d,
                        )*
                    }
                }
            }

            impl serde::Serialize for ProxyTuningParams {
                fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
                where
                    S: serde::Serializer,
                {
                    use serde::ser::SerializeMap;
                    let mut m = serializer.serialize_map(None)?;
                    $(
                        m.serialize_entry(
                            stringify!($i),
                            &format!("{}", &self.$i),
                        )?;
                    )*
                    m.end()
                }
            }

            impl<'de> serde::Deserialize<'de> for ProxyTuningParams {
                fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
                where
                    D: serde::Deserializer<'de>,
                {
                    let result = <HashMap<String, String>>::deserialize(deserializer)?;
                    let mut out = ProxyTuningParams::default();
                    for (k, v) in result.into_iter() {
                        match k.as_str() {
                            $(
                                stringify!($i) => match v.parse::<$t>() {
                                    Ok(v) => out.$i = v,
                                    Err(e) => tracing::warn!(param = %k, %e, "ignoring unparsable tuning param"),
                                },
                            )*
                            _ => tracing::warn!(param = %k, "ignoring unknown tuning param"),
                        }
                    }
                    Ok(out)
                }
            }
        };
    }

    mk_tune! {
        /// How long a peer asking for a lock may make us wait while we pull
        /// the lock towards ourselves first. [Default: 5s]
        local_lock_wait_ms: u64 = 1000 * 5,

        /// Timeout for obtaining replicas when the caller does not give one.
        /// [Default: 30s]
        default_obtain_timeout_ms: u64 = 1000 * 30,

        /// How long a proxy lease lasts after the last message read from the
        /// peer. Zero means leases never expire. [Default: 0]
        proxy_lease_ms: u64 = 0,
    }

    impl ProxyTuningParams {
        /// Wait bound for local lock acquisition on behalf of a peer.
        pub fn local_lock_wait(&self) -> std::time::Duration {
            std::time::Duration::from_millis(self.local_lock_wait_ms)
        }

        /// Lease extension applied on every read, `None` if leases never expire.
        pub fn lease_duration_ms(&self) -> Option<u64> {
            if self.proxy_lease_ms == 0 {
                None
            } else {
                Some(self.proxy_lease_ms)
            }
        }
    }
}

/// Tuning params shared by a manager and all of its proxies.
pub type ProxyTuningParams = std::sync::Arc<tuning_params_struct::ProxyTuningParams>;

/// A fresh default obtain timeout starting now.
pub fn default_obtain_timeout(tuning_params: &ProxyTuningParams) -> ProxyTimeout {
    ProxyTimeout::from_millis(tuning_params.default_obtain_timeout_ms)
}
