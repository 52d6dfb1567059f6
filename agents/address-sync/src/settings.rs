//! Configuration

use roda_base::decl_settings;

decl_settings!(AddressSync {});
