/*
Copyright 2026  The nicq Authors.

Licensed under the Apache License, Version 2.0 (the "License");
you may not use this file except in compliance with the License.
You may obtain a copy of the License at

    http://www.apache.org/licenses/LICENSE-2.0

Unless required by applicable law or agreed to in writing, software
distributed under the License is distributed on an "AS IS" BASIS,
WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
See the License for the specific language governing permissions and
limitations under the License.
*/

/// Crate-internal trait for defining metrics.
pub(crate) trait NamedMetric {
    /// The name of the metric.
    fn name(&self) -> &'static str;
    /// The description of the metric.
    fn description(&self) -> &'static str;
    /// The unit of the metric.
    fn unit(&self) -> metrics::Unit;
    /// The label key and value attached to each sample.
    fn label(&self) -> (&'static str, &'static str);
}

/// Defines labelled counters.
///
/// Every variant carries exactly one `&'static str` label; the field name is
/// the label key. The generated `emit` describes each variant to the
/// recorder once and then increments the counter by one.
#[macro_export]
macro_rules! define_counters {
    (
        $metric_type:ident {
            $(
                $variant:ident { $label:ident } => {
                    name: $name:expr,
                    description: $description:expr,
                    unit: $unit:expr $(,)?
                }
            ),* $(,)?
        }
    ) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        #[allow(dead_code)]
        pub(crate) enum $metric_type {
            $(
                $variant { $label: &'static str }
            ),*
        }

        impl $crate::metrics::metrics_macro::NamedMetric for $metric_type {
            fn name(&self) -> &'static str {
                match self {
                    $(
                        Self::$variant { .. } => $name,
                    )*
                }
            }

            fn description(&self) -> &'static str {
                match self {
                    $(
                        Self::$variant { .. } => $description,
                    )*
                }
            }

            fn unit(&self) -> metrics::Unit {
                match self {
                    $(
                        Self::$variant { .. } => $unit,
                    )*
                }
            }

            fn label(&self) -> (&'static str, &'static str) {
                match self {
                    $(
                        Self::$variant { $label } => (stringify!($label), *$label),
                    )*
                }
            }
        }

        impl $crate::metrics::EmittableMetric for $metric_type {
            fn emit(self) {
                use $crate::metrics::metrics_macro::NamedMetric;

                let name = self.name();
                let unit = self.unit();
                let description = self.description();
                let (key, value) = self.label();

                match self {
                    $(
                        Self::$variant { .. } => {
                            // Describe each metric variant only once
                            static DESCRIBE: std::sync::Once = std::sync::Once::new();
                            DESCRIBE.call_once(|| {
                                metrics::describe_counter!(name, unit, description);
                            });
                        }
                    )*
                }

                metrics::counter!(name, key => value).increment(1);
            }
        }
    };
}
