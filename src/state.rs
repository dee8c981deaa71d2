use std::sync::Arc;

use crate::{
    cart::CartLedger,
    catalog::Catalog,
    config::Config,
    gateway::{DarajaGateway, PushGateway},
    notify::{LogNotifier, Notifier},
    payments::PaymentStore,
};

pub struct State {
    pub config: Config,
    pub catalog: Catalog,
    pub carts: CartLedger,
    pub payments: PaymentStore,
    pub gateway: Box<dyn PushGateway>,
    pub notifier: Box<dyn Notifier>,
}

impl State {
    pub fn new(config: Config) -> Arc<Self> {
        let gateway = DarajaGateway::new(config.mpesa.clone());

        Arc::new(Self {
            config,
            catalog: Catalog::new(),
            carts: CartLedger::new(),
            payments: PaymentStore::new(),
            gateway: Box::new(gateway),
            notifier: Box::new(LogNotifier),
        })
    }
}

#[cfg(test)]
impl State {
    pub fn for_tests(mpesa: crate::config::MpesaConfig, gateway: Box<dyn PushGateway>) -> Arc<Self> {
        Self::for_tests_with_notifier(mpesa, gateway, Box::new(LogNotifier))
    }

    pub fn for_tests_with_notifier(
        mpesa: crate::config::MpesaConfig,
        gateway: Box<dyn PushGateway>,
        notifier: Box<dyn Notifier>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config: Config { port: 0, mpesa },
            catalog: Catalog::new(),
            carts: CartLedger::new(),
            payments: PaymentStore::new(),
            gateway,
            notifier,
        })
    }
}
