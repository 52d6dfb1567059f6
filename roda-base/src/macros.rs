use serde::de::DeserializeOwned;

/// Export this so callers don't need to import paste themselves.
#[doc(hidden)]
pub use paste;

use crate::settings::{load_settings, Settings};

#[macro_export]
/// Declare a new settings block for an agent.
///
/// The generated struct flattens the shared [`crate::Settings`] and adds the
/// listed fields. Integers must be declared as `String` so they can be set
/// through env vars; agents parse them in `from_settings`.
///
/// ### Usage
///
/// ```ignore
/// decl_settings!(Transformer {
///     datasettype: String,
///     date: Option<String>,
/// });
/// ```
macro_rules! decl_settings {
    (
        $name:ident {
            $($(#[$tags:meta])* $prop:ident: $type:ty,)*
        }
    ) => {
        roda_base::macros::paste::paste! {
            #[derive(Debug, serde::Deserialize)]
            #[serde(rename_all = "camelCase")]
            #[doc = "Settings for `" $name "`"]
            pub struct [<$name Settings>] {
                #[serde(flatten)]
                pub(crate) base: roda_base::Settings,
                $(
                    $(#[$tags])*
                    pub(crate) $prop: $type,
                )*
            }

            impl std::ops::Deref for [<$name Settings>] {
                type Target = roda_base::Settings;

                fn deref(&self) -> &Self::Target {
                    &self.base
                }
            }

            impl AsRef<roda_base::Settings> for [<$name Settings>] {
                fn as_ref(&self) -> &roda_base::Settings {
                    &self.base
                }
            }

            impl roda_base::NewFromSettings for [<$name Settings>] {
                type Error = eyre::Report;

                fn new() -> Result<Self, Self::Error> {
                    roda_base::macros::_new_settings(stringify!($name))
                }
            }
        }
    }
}

/// Static logic called by the `decl_settings!` macro. Do not call directly.
#[doc(hidden)]
pub fn _new_settings<T>(name: &str) -> eyre::Result<T>
where
    T: DeserializeOwned + AsRef<Settings>,
{
    load_settings::<T>(name)
}
