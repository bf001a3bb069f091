/*!
# Parc DevKit - Fixtures et Utilitaires pour Développement

Bibliothèque facilitant les tests du kernel Parc avec:
- Fixtures d'inventaire polymorphe (assets, VMs, hôtes cloud, clusters)
- Snapshots JSON directement chargeables par le store du kernel
- Seeds d'environnement de dev écrites sur disque
*/

pub mod fixtures;

pub use fixtures::InventoryFixture;

/// Initialise le logging pour les tests (idempotent).
pub fn init_test_logging() {
    env_logger::try_init().ok();
}
