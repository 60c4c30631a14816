mod tests_rates;
