//! Template functions that live in the service container.
//!
//! A [`ServiceFunction`] holds a lookup handle and a service id rather than
//! the function itself, so swapping the service changes what templates call.

use std::{collections::HashMap, sync::Arc};

use tera::Value;

use crate::container::{Service, ServiceLookup};

/// A shared tera function, as stored in the container.
pub type TemplateFunction = Arc<dyn tera::Function>;

/// Wraps `function` as a container service that a [`ServiceFunction`] can find.
pub fn function_service(function: impl tera::Function + 'static) -> Service {
    let function: TemplateFunction = Arc::new(function);
    Service::new(function)
}

/// A tera function that fetches its implementation from the container on
/// every call.
pub struct ServiceFunction {
    lookup: Arc<dyn ServiceLookup>,
    service: String,
}

impl ServiceFunction {
    pub fn new(lookup: Arc<dyn ServiceLookup>, service: impl Into<String>) -> Self {
        Self {
            lookup,
            service: service.into(),
        }
    }
}

impl tera::Function for ServiceFunction {
    fn call(&self, args: &HashMap<String, Value>) -> tera::Result<Value> {
        let function = self
            .lookup
            .get(&self.service)
            .and_then(|service| service.cloned::<TemplateFunction>(&self.service))
            .map_err(|e| {
                tera::Error::chain(
                    format!("resolving template function `{}`", self.service),
                    e,
                )
            })?;
        function.call(args)
    }
}

#[cfg(test)]
mod test {
    use std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicU64, Ordering},
            Arc,
        },
    };

    use tera::{Function, Value};

    use super::{function_service, ServiceFunction};
    use crate::container::{Container, Service};

    fn greeting(text: &'static str) -> impl Function {
        move |_: &HashMap<String, Value>| -> tera::Result<Value> { Ok(Value::from(text)) }
    }

    #[test]
    fn replaced_service_changes_behaviour() {
        let mut container = Container::new();
        container.set("greet", function_service(greeting("hello")));
        let container = Arc::new(container);

        let function = ServiceFunction::new(container.clone(), "greet");
        assert_eq!(function.call(&HashMap::new()).unwrap(), "hello");

        let mut replaced = (*container).clone();
        replaced.set("greet", function_service(greeting("goodbye")));
        let function = ServiceFunction::new(Arc::new(replaced), "greet");
        assert_eq!(function.call(&HashMap::new()).unwrap(), "goodbye");
    }

    #[test]
    fn factory_backed_service_is_fetched_per_call() {
        let counter = Arc::new(AtomicU64::new(0));
        let calls = counter.clone();
        let mut container = Container::new();
        container.set_factory("tick", move |_| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok(function_service(
                move |_: &HashMap<String, Value>| -> tera::Result<Value> { Ok(Value::from(n)) },
            ))
        });

        let function = ServiceFunction::new(Arc::new(container), "tick");
        assert_eq!(function.call(&HashMap::new()).unwrap(), 0);
        assert_eq!(function.call(&HashMap::new()).unwrap(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_or_mistyped_service_fails_the_call() {
        let mut container = Container::new();
        container.set("number", Service::new(3i32));
        let container = Arc::new(container);

        let missing = ServiceFunction::new(container.clone(), "absent");
        assert!(missing.call(&HashMap::new()).is_err());

        let mistyped = ServiceFunction::new(container, "number");
        let err = mistyped.call(&HashMap::new()).unwrap_err();
        assert_eq!(err.to_string(), "resolving template function `number`");
    }
}
